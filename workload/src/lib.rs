//! MapReduce applications that link against the executor library.

pub mod wordcount;
