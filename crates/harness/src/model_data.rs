//! Embedded model
//!
//! The serialized example network, written by the build script and linked
//! into the read-only data of the library.

const MODEL_LEN: usize = include_bytes!(concat!(env!("OUT_DIR"), "/example_model.bin")).len();

// Bare-metal linker scripts place this section in flash
#[cfg_attr(target_os = "none", link_section = ".model_data")]
static MODEL_BYTES: [u8; MODEL_LEN] =
    *include_bytes!(concat!(env!("OUT_DIR"), "/example_model.bin"));

/// Serialized example network
pub static EXAMPLE_MODEL: &[u8] = &MODEL_BYTES;

#[cfg(test)]
mod tests {
    use super::*;
    use micro_engine::{Model, SCHEMA_VERSION};

    #[test]
    fn test_embedded_model_matches_schema() {
        let model = Model::map(EXAMPLE_MODEL);
        assert_eq!(model.version(), SCHEMA_VERSION);
        assert_eq!(model.decode().unwrap(), micro_engine::example_lstm_model());
    }
}
