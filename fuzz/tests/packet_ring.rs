//! Bolero fuzzer for the in-memory packet ring.
//!
//! Properties tested:
//! - Delivery is strictly in allocation order, committed or not
//! - The tail only advances over released slots
//! - A slot cannot be released twice, even after reuse
//! - Occupancy and per-state counts always match the model

use bolero::check;
use tunring_fuzz::ring_model::{execute_and_verify, RingOp};

fn main() {
    check!()
        .with_type::<(u8, Vec<RingOpInput>)>()
        .for_each(|(capacity, ops)| {
            let ops: Vec<RingOp> = ops.iter().map(|op| op.to_ring_op()).collect();

            if let Err(e) = execute_and_verify(*capacity as u32, &ops) {
                panic!("Invariant violated: {}", e);
            }
        });
}

/// Fuzz-friendly input type for ring operations.
#[derive(Debug, Clone, bolero::TypeGenerator)]
enum RingOpInput {
    Alloc { len: u16, tag: u8 },
    Commit { pick: u8 },
    Pop,
    Release { pick: u8 },
    ReleaseStale { pick: u8 },
}

impl RingOpInput {
    fn to_ring_op(&self) -> RingOp {
        match *self {
            RingOpInput::Alloc { len, tag } => RingOp::Alloc { len, tag },
            RingOpInput::Commit { pick } => RingOp::Commit { pick },
            RingOpInput::Pop => RingOp::Pop,
            RingOpInput::Release { pick } => RingOp::Release { pick },
            RingOpInput::ReleaseStale { pick } => RingOp::ReleaseStale { pick },
        }
    }
}
