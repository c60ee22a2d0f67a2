//! Interactive terminal chat against the active session.
//!
//! Runs turns in-process through the same runtime the WebSocket channel
//! uses and folds the frames through the client transcript, so the terminal
//! shows exactly what a browser client would. Entry point:
//! `loop_runner::run_chat_loop`.

pub mod banner;
pub mod commands;
pub mod input;
pub mod loop_runner;
pub mod renderer;
