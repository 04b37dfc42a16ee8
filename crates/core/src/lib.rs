pub mod consumption;
pub mod period;
pub mod reading;

pub use consumption::{aggregate, AggregateError, Aggregator, PeriodSummary, RolloverPolicy};
pub use period::{parse_instant, Bound, BoundPolicy, BoundSide, InstantRange, Period, RangeFilter};
pub use reading::Reading;
