pub mod dead_letter_queue;
pub mod manager;
pub mod retry_processor;
pub mod retry_queue;
pub mod task_queue;

pub use dead_letter_queue::DeadLetterQueue;
pub use manager::QueueManager;
pub use retry_processor::RetryProcessor;
pub use retry_queue::RetryQueue;
pub use task_queue::TaskQueue;

fn queue_key(name: &str) -> String {
    format!("{name}:queue")
}

fn inflight_key(name: &str) -> String {
    format!("{name}:inflight")
}

fn message_key(name: &str, message_id: &str) -> String {
    format!("{name}:messages:{message_id}")
}

fn retry_key(name: &str) -> String {
    format!("{name}:retry")
}

fn dlq_key(name: &str) -> String {
    format!("{name}:dlq")
}

fn dlq_reasons_key(name: &str) -> String {
    format!("{name}:dlq:reasons")
}

fn stats_key(name: &str) -> String {
    format!("{name}:stats")
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn now_unix_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

pub(crate) fn random_hex(len: usize) -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}
