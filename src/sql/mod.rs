//! SQL text assembly: fragments, SELECT/CTE builders, link expansion, and
//! the DDL catalog installed at setup time.

pub mod fragment;
pub mod functions;
pub mod link_expansion;
pub mod select;
