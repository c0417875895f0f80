/// Overlay text stamped across the exam page so captures can be traced back
/// to a student and attempt.
pub fn watermark_text(telegram_id: Option<i64>, attempt_id: i64, ts: &str) -> String {
    let tid = telegram_id
        .filter(|id| *id != 0)
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!("Examly • tid:{} • attempt:{} • {}", tid, attempt_id, ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_every_identifier() {
        assert_eq!(
            watermark_text(Some(777), 31, "2025-05-01T08:00:00.000Z"),
            "Examly • tid:777 • attempt:31 • 2025-05-01T08:00:00.000Z"
        );
    }

    #[test]
    fn unknown_telegram_id() {
        assert_eq!(watermark_text(None, 4, "now"), "Examly • tid:unknown • attempt:4 • now");
        assert_eq!(watermark_text(Some(0), 4, "now"), "Examly • tid:unknown • attempt:4 • now");
    }
}
