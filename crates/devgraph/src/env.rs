use std::env;
use std::sync::OnceLock;

static DEVGRAPH_FORCE_EAGER: OnceLock<bool> = OnceLock::new();
static DEVGRAPH_GRAPH_CACHE_CAPACITY: OnceLock<Option<usize>> = OnceLock::new();
static DEVGRAPH_FALLBACK: OnceLock<Option<String>> = OnceLock::new();
static DEVGRAPH_SIGNATURE_POLICY: OnceLock<Option<String>> = OnceLock::new();
static DEVGRAPH_ALLOW_BLAS_CAPTURE: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_bool(name: &str) -> bool {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    }
}

fn read_lowercase(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_ascii_lowercase()),
        _ => None,
    }
}

/// `DEVGRAPH_FORCE_EAGER`: capturing converters behave like the eager converter.
pub(crate) fn force_eager() -> bool {
    *DEVGRAPH_FORCE_EAGER.get_or_init(|| read_bool("DEVGRAPH_FORCE_EAGER"))
}

/// `DEVGRAPH_GRAPH_CACHE_CAPACITY`: per-function graph cache size. Zero and junk are ignored.
pub(crate) fn graph_cache_capacity() -> Option<usize> {
    *DEVGRAPH_GRAPH_CACHE_CAPACITY.get_or_init(|| {
        env::var("DEVGRAPH_GRAPH_CACHE_CAPACITY")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|&value| value > 0)
    })
}

/// `DEVGRAPH_FALLBACK`: `eager` or `error`.
pub(crate) fn fallback_policy() -> Option<&'static str> {
    DEVGRAPH_FALLBACK
        .get_or_init(|| read_lowercase("DEVGRAPH_FALLBACK"))
        .as_deref()
}

/// `DEVGRAPH_SIGNATURE_POLICY`: `strict` or `recapture`.
pub(crate) fn signature_policy() -> Option<&'static str> {
    DEVGRAPH_SIGNATURE_POLICY
        .get_or_init(|| read_lowercase("DEVGRAPH_SIGNATURE_POLICY"))
        .as_deref()
}

/// `DEVGRAPH_ALLOW_BLAS_CAPTURE`: initial value of the process-wide BLAS capture flag.
pub(crate) fn allow_blas_capture() -> bool {
    *DEVGRAPH_ALLOW_BLAS_CAPTURE.get_or_init(|| read_bool("DEVGRAPH_ALLOW_BLAS_CAPTURE"))
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("1"));
        assert!(parse_bool(" TRUE "));
        assert!(parse_bool("on"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }
}
