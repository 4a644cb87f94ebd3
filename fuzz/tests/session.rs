//! Bolero fuzzer for session packet flow over the in-memory driver.
//!
//! Properties tested:
//! - Packets reach each side intact and in order
//! - A full ring is reported, never overwritten
//! - Every received packet is released exactly once
//! - Abandoned send buffers go out zeroed
//! - Shutdown is sticky for new operations
//! - Counters match what actually moved

use bolero::check;
use tunring_fuzz::session_model::{execute_and_verify, SessionOp};

fn main() {
    check!()
        .with_type::<(u8, Vec<SessionOpInput>)>()
        .for_each(|(capacity, ops)| {
            let ops: Vec<SessionOp> = ops.iter().map(|op| op.to_session_op()).collect();

            if let Err(e) = execute_and_verify(*capacity as u32, &ops) {
                panic!("Invariant violated: {}", e);
            }
        });
}

/// Fuzz-friendly input type for session operations.
#[derive(Debug, Clone, bolero::TypeGenerator)]
enum SessionOpInput {
    Inject { len: u16, tag: u8 },
    Receive,
    ReleaseHeld { pick: u8 },
    RecvInto { buf_len: u16 },
    Send { len: u16, tag: u8 },
    Allocate { len: u16, tag: u8 },
    SendHeld { pick: u8 },
    DropHeld { pick: u8 },
    Drain,
    Shutdown,
}

impl SessionOpInput {
    fn to_session_op(&self) -> SessionOp {
        match *self {
            SessionOpInput::Inject { len, tag } => SessionOp::Inject { len, tag },
            SessionOpInput::Receive => SessionOp::Receive,
            SessionOpInput::ReleaseHeld { pick } => SessionOp::ReleaseHeld { pick },
            SessionOpInput::RecvInto { buf_len } => SessionOp::RecvInto { buf_len },
            SessionOpInput::Send { len, tag } => SessionOp::Send { len, tag },
            SessionOpInput::Allocate { len, tag } => SessionOp::Allocate { len, tag },
            SessionOpInput::SendHeld { pick } => SessionOp::SendHeld { pick },
            SessionOpInput::DropHeld { pick } => SessionOp::DropHeld { pick },
            SessionOpInput::Drain => SessionOp::Drain,
            SessionOpInput::Shutdown => SessionOp::Shutdown,
        }
    }
}
