/// Upstream API endpoints. The base is overridable per backend instance
/// so tests and alternate deployments can point elsewhere.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Model used for plain streaming completions and fallbacks.
pub const COMPLETION_MODEL: &str = "gpt-4";

/// Generation temperatures: the "detailed mode" flag raises sampling
/// temperature for longer, more discursive answers.
pub const TEMPERATURE_BASE: f32 = 0.2;
pub const TEMPERATURE_DETAILED: f32 = 0.7;

/// Confirmed-source mode: the finally-chosen answer text is re-chunked
/// into slices of this many characters and emitted as synthetic deltas.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Pause between synthetic deltas, to present a plausible stream for an
/// answer that was not itself streamed.
pub const SYNTHETIC_DELAY_MS: u64 = 30;

/// Run polling cadence and bound for confirmed-source mode. The bound is
/// ours; the upstream contract has no terminal-state guarantee.
pub const POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_MAX_POLLS: u32 = 60;

/// System instruction for file-grounded requests. The attached document
/// body is appended after this preamble.
pub const FILE_GROUNDED_PREAMBLE: &str = "You are a helpful assistant. Answer using only the \
     following document as your knowledge source. If the document does not contain the answer, \
     say so.\n\nDocument:\n";

/// Placeholder reference returned by the image-intent short-circuit.
pub const IMAGE_PLACEHOLDER_URL: &str = "/placeholder.svg?height=512&width=512";
pub const IMAGE_REPLY_TEXT: &str = "I've generated this image based on your request:";

/// Status codes worth one more attempt on the initial upstream call.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

/// Upstream SSE line length cap (1 MB), matching the relay's tolerance
/// for oversized provider chunks.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;
