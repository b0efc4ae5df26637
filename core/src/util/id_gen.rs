use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use uuid::Uuid;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Format: exec-{YYYYMMDDHHmmss}-{seq}-{random8}
///
/// The process-wide sequence keeps ids unique even when the clock and the
/// random suffix collide.
pub fn generate_execution_id() -> String {
    let ts = Local::now().format("%Y%m%d%H%M%S");
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let uuid = Uuid::new_v4().simple().to_string();
    let suffix = &uuid[..8];
    format!("exec-{}-{}-{}", ts, seq, suffix)
}
