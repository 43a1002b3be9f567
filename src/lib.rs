pub mod api;
pub mod core;
pub mod frame_extractor;

use once_cell::sync::OnceCell;

static LOGGER: OnceCell<()> = OnceCell::new();

/// 初始化日志，多次调用只生效一次
pub fn init_logging() {
    LOGGER.get_or_init(|| {
        #[cfg(target_os = "android")]
        {
            android_logger::init_once(
                android_logger::Config::default()
                    .with_max_level(log::LevelFilter::Debug)
                    .with_tag("video_label_lib"),
            );
        }

        #[cfg(not(target_os = "android"))]
        {
            // RUST_LOG overrides the default level
            let _ = env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or("info"),
            )
            .try_init();
        }
    });
}
