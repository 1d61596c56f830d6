pub mod cache_warmer;

pub use cache_warmer::{
    BackgroundWarmer, StaticTenantDirectory, TenantDirectory, WarmCycleReport, WarmTask,
    WarmerState,
};
