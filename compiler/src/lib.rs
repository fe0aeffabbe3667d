// ccc — Collective Communication Compiler
//
// Middle-end for lowering GPU collective-communication algorithms into
// per-rank, per-execution-unit instruction schedules.

pub mod buffer;
pub mod dag;
pub mod diag;
pub mod dot;
pub mod fuse;
pub mod infer;
pub mod ir;
pub mod lower;
pub mod meta;
pub mod pass;
pub mod pipeline;
pub mod replicate;
