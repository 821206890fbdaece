//! Background actors of the hub
//!
//! Each actor runs as an independent async task and is controlled through a
//! cloneable handle that sends commands over an mpsc channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!   reporters ──► Ingestor ──┬──► StatusCache ◄──── EvaluatorActor (tick)
//!                            │         │                  │
//!                            └──► PendingWriteBuffer ◄────┘
//!                                      │
//!                                 WriterActor (tick) ──► StatusStore
//! ```
//!
//! ## Actors
//!
//! - **EvaluatorActor**: drives the liveness state machine on a fixed
//!   interval, runs the never-reported sweep and allow-list cleanup
//! - **WriterActor**: persists the write-back buffer on a fixed interval
//!
//! ## Shutdown
//!
//! `shutdown()` on a handle waits until the actor has stopped; the writer
//! flushes pending updates before it does.

pub mod evaluator;
pub mod messages;
pub mod writer;
