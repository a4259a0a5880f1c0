pub mod env;
pub mod telemetry;

/// Compares two `&str`s without short-circuiting on the first mismatched byte, so the time taken
/// doesn't leak how much of a presented token was correct
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let res = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (l, r)| {
            acc | (std::hint::black_box(*l) ^ std::hint::black_box(*r))
        });

    res == 0
}
