// Snowflake-style i64 id generation, replacing the legacy schema's
// `noetl.snowflake_id()` Postgres sequence function with an in-process
// generator so id allocation doesn't round-trip through the database.
//
// Layout (mirrors the legacy function's bit widths): 1 unused sign bit,
// 41 bits milliseconds since EPOCH, 10 bits node id, 12 bits per-ms
// sequence.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const EPOCH_MS: i64 = 1_700_000_000_000;
const NODE_BITS: i64 = 10;
const SEQ_BITS: i64 = 12;
const MAX_NODE_ID: i64 = (1 << NODE_BITS) - 1;
const MAX_SEQ: i64 = (1 << SEQ_BITS) - 1;

struct GeneratorState {
    last_ms: i64,
    sequence: i64,
}

pub struct SnowflakeGenerator {
    node_id: i64,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator {
    pub fn new(node_id: i64) -> Self {
        assert!(
            (0..=MAX_NODE_ID).contains(&node_id),
            "node_id must be in 0..={MAX_NODE_ID}"
        );
        Self {
            node_id,
            state: Mutex::new(GeneratorState {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    /// Builds a generator from `NOETL_NODE_ID`, defaulting to 0.
    pub fn from_env() -> Self {
        let node_id = std::env::var("NOETL_NODE_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Self::new(node_id)
    }

    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().expect("snowflake generator poisoned");
        let mut now = current_millis();

        if now < state.last_ms {
            // Clock moved backwards; stall until it catches up rather than
            // risk emitting a duplicate id.
            while now < state.last_ms {
                now = current_millis();
            }
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQ;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    now = current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }

        state.last_ms = now;

        ((now - EPOCH_MS) << (NODE_BITS + SEQ_BITS))
            | (self.node_id << SEQ_BITS)
            | state.sequence
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonically_increasing() {
        let gen = SnowflakeGenerator::new(1);
        let mut prev = gen.next_id();
        for _ in 0..1000 {
            let id = gen.next_id();
            assert!(id > prev);
            prev = id;
        }
    }

    #[test]
    fn ids_from_different_nodes_do_not_collide() {
        let gen_a = SnowflakeGenerator::new(1);
        let gen_b = SnowflakeGenerator::new(2);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            assert!(seen.insert(gen_a.next_id()));
            assert!(seen.insert(gen_b.next_id()));
        }
    }

    #[test]
    #[should_panic]
    fn node_id_out_of_range_panics() {
        SnowflakeGenerator::new(MAX_NODE_ID + 1);
    }
}
