pub mod backend;
pub mod backtrace;
pub mod clock;
pub mod codec;
pub mod context;
pub mod error;
pub mod frontend;
pub mod level;
pub mod logger;
pub mod queue;
pub mod record;
pub mod sink;
pub mod transit;

pub use backend::{Backend, BackendOptions, BackendStats};
pub use clock::ClockSource;
pub use error::{ErrorEvent, QuillError};
pub use frontend::{Frontend, FrontendOptions, HugePagesPolicy, LoggerHandle};
pub use level::{EventKind, Level, MacroMetadata};
pub use queue::QueueType;
pub use sink::{ConsoleSink, Filter, FilterChain, NullSink, Sink, SinkCore};
