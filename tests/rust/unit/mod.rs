//! Unit tests that exercise the public compiler surface without a
//! database.

mod compile_tests;
mod projection_tests;
mod slug_tests;
