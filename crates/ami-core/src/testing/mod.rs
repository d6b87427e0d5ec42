//! Testing utilities for deterministic driver tests without a real `reduce`.

pub mod mock_tool;

pub use mock_tool::MockTool;
