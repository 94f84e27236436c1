//! Consumer-side time series: samples, the store, simplification and views.
//!
//! Data flows one way:
//!
//! ```text
//! broker delivery / history table
//!        │  SampleAdapter (timestamp unit, key scope)
//!        ▼
//!   StoreWorker ── write lock ──► TimeSeriesStore ── ChangeEvent ──► LiveView
//!                                        ▲                              │
//!                                        └──── read lock, memoized ◄────┘
//! ```

pub mod adapter;
pub mod clock;
pub mod frame;
pub mod mask;
pub mod sample;
pub mod simplify;
pub mod store;
pub mod view;
pub mod worker;

pub use adapter::{parse_delivery, HistoricalTable, KeyScope, SampleAdapter, TimestampUnit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use frame::FrameScheduler;
pub use mask::TimeMask;
pub use sample::{KeyedSample, MinAndMax, Sample, SeriesKey, TimeValue};
pub use simplify::{simplify, simplify_to_max_points, stride_sample, SimplifyOptions};
pub use store::{
    ChangeEvent, DuplicatePolicy, SharedStore, StoreOptions, StoreStats, TimeSeriesStore,
};
pub use view::{LiveView, LiveViewHandle, LogSink, RenderFrame, RenderSink};
pub use worker::{StoreCommand, StoreWorker, StoreWorkerHandle};
