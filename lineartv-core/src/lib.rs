pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;

pub use catalog::{
    CatalogError, CatalogResult, CatalogStore, ChannelRecord, CurrentMovie, Movie, ScheduleRow,
};
pub use config::{
    load_lineartv_config, LinearTvConfig, PathsSection, TranscoderSection, TuningSection,
};
pub use engine::process::{
    CommandExecutor, SpawnExecutor, SystemCommandExecutor, SystemSpawnExecutor,
};
pub use engine::publisher::{PublishError, SlotPublisher, PUBLIC_MASTER, PUBLIC_STREAM};
pub use engine::readiness::{segment_refs, slot_is_playable, ReadinessDetector};
pub use engine::schedule::{format_wat, DurationProber, FfprobeProber, ScheduleProjector};
pub use engine::slot::Slot;
pub use engine::supervisor::{
    SupervisorError, TranscodeEvent, TranscodeRole, TranscodeSpec, TranscoderHandle,
    TranscoderSupervisor,
};
pub use engine::{
    ChannelEngine, ChannelHandle, ChannelRuntime, ChannelStatus, EngineError, EngineResult,
    QueueRow,
};
pub use error::{ConfigError, Result};
pub use registry::{ChannelRegistry, RegistryError, RegistryResult};
