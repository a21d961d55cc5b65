//! C FFI of the exynos-mfc crate.
//!
//! This crate exposes the decoder and encoder contexts as versioned operation tables, obtained
//! with [`decoder::exynos_mfc_decoder_ops`] and [`encoder::exynos_mfc_encoder_ops`]. Every
//! operation returns one of the `MFC_ERROR_*` codes unless documented otherwise.

/// Run `$body` on the pool of `$ctx` designated by the C direction `$dir`.
macro_rules! with_pool {
    ($ctx:expr, $dir:expr, |$pool:ident| $body:expr) => {
        match $dir {
            $crate::common::MFC_DIRECTION_INPUT => {
                let $pool = $ctx.input();
                $body
            }
            $crate::common::MFC_DIRECTION_OUTPUT => {
                let $pool = $ctx.output();
                $body
            }
            _ => Err(exynos_mfc::VideoError::BadParam("invalid direction")),
        }
    };
}

pub mod buffer;
pub mod common;
pub mod decoder;
pub mod encoder;

static INIT: std::sync::Once = std::sync::Once::new();

/// Initialize the library. This only sets up the proper hooks for logging, so although it is not
/// a hard requirement to call this function, failure to do so will result in no logs being
/// printed.
#[no_mangle]
pub extern "C" fn exynos_mfc_init() {
    INIT.call_once(|| {
        #[cfg(feature = "env_logger")]
        env_logger::builder().format_timestamp(None).init();

        #[cfg(feature = "android")]
        android_logger::init_once(
            android_logger::Config::default().with_min_level(log::Level::Trace),
        );
    });
}
