use crate::traits::ParseOutput;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters a front end accumulates over its parse passes.
///
/// One file is usually parsed several times (once per macro context it is
/// included with), so everything here counts passes, not files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserMetrics {
    pub passes_attempted: usize,
    pub passes_failed: usize,

    #[serde(with = "duration_millis")]
    pub total_parse_time: Duration,

    pub total_declarations: usize,

    /// Include directives evaluated in active code, nested ones included
    pub total_includes: usize,

    /// Bytes of the parsed files found inside inactive blocks
    pub inactive_bytes: usize,

    /// Syntax errors tolerated during declaration extraction
    pub syntax_errors: usize,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

impl ParserMetrics {
    /// Account for one pass. `output` is `None` when the pass failed.
    pub fn record(&mut self, output: Option<&ParseOutput>, elapsed: Duration) {
        self.passes_attempted += 1;
        self.total_parse_time += elapsed;
        match output {
            Some(output) => {
                self.total_declarations += output.declarations.len();
                self.total_includes += output.includes.len();
                self.inactive_bytes += output.inactive_blocks.iter().map(|b| b.len()).sum::<usize>();
                self.syntax_errors += output.error_count;
            }
            None => self.passes_failed += 1,
        }
    }

    pub fn passes_succeeded(&self) -> usize {
        self.passes_attempted - self.passes_failed
    }

    /// Share of passes that produced an output, 0.0 when nothing ran
    pub fn success_rate(&self) -> f64 {
        if self.passes_attempted == 0 {
            return 0.0;
        }
        self.passes_succeeded() as f64 / self.passes_attempted as f64
    }

    /// Mean wall time of a pass, failed ones included
    pub fn avg_parse_time(&self) -> Duration {
        match u32::try_from(self.passes_attempted) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_parse_time / n,
        }
    }

    pub fn merge(&mut self, other: &ParserMetrics) {
        self.passes_attempted += other.passes_attempted;
        self.passes_failed += other.passes_failed;
        self.total_parse_time += other.total_parse_time;
        self.total_declarations += other.total_declarations;
        self.total_includes += other.total_includes;
        self.inactive_bytes += other.inactive_bytes;
        self.syntax_errors += other.syntax_errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::TextRange;

    #[test]
    fn test_record_passes() {
        let mut metrics = ParserMetrics::default();
        let output = ParseOutput {
            inactive_blocks: vec![TextRange::new(10, 30), TextRange::new(50, 55)],
            error_count: 1,
            ..Default::default()
        };
        metrics.record(Some(&output), Duration::from_millis(20));
        metrics.record(None, Duration::from_millis(10));

        assert_eq!(metrics.passes_attempted, 2);
        assert_eq!(metrics.passes_succeeded(), 1);
        assert_eq!(metrics.inactive_bytes, 25);
        assert_eq!(metrics.syntax_errors, 1);
        assert_eq!(metrics.success_rate(), 0.5);
        assert_eq!(metrics.avg_parse_time(), Duration::from_millis(15));
    }

    #[test]
    fn test_merge_and_serialize() {
        let mut a = ParserMetrics::default();
        a.record(None, Duration::from_millis(4));
        let mut b = ParserMetrics::default();
        b.record(Some(&ParseOutput::default()), Duration::from_millis(6));
        a.merge(&b);
        assert_eq!(a.passes_attempted, 2);
        assert_eq!(a.passes_failed, 1);

        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"total_parse_time\":10"));
        let back: ParserMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_empty_metrics() {
        let m = ParserMetrics::default();
        assert_eq!(m.success_rate(), 0.0);
        assert_eq!(m.avg_parse_time(), Duration::ZERO);
    }
}
