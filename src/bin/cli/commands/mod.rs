pub mod deck;
pub mod due;
pub mod grade;
pub mod interleave;
pub mod preview;
pub mod sync;
