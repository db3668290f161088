//! Process hosts that drive a session outside a real media room.

pub mod stdio;
