#[macro_use]
pub mod log;

pub mod config;
pub mod corpus;
pub mod depgraph;
pub mod distill;
pub mod error;
pub mod ir;
pub mod memtrack;
pub mod prog;
pub mod rescache;
pub mod scanner;
pub mod seed;
pub mod target;
pub mod textlexer;
pub mod trace_tree;
pub mod translate;
pub mod variant;
