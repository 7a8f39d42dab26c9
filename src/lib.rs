//! Configure and drive LED-485 seven-segment displays over Modbus RTU or Modbus TCP.

pub mod codec;
pub mod commands;
pub mod connection;
pub mod dispatch;
pub mod output;
pub mod registers;
