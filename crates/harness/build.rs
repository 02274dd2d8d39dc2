//! Build script for the execution harness
//!
//! Serializes the example network into OUT_DIR so the library can embed it.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Rerun when the network definition or the model format changes
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../micro-engine/src/builder.rs");
    println!("cargo:rerun-if-changed=../micro-engine/src/model.rs");
    println!("cargo:rerun-if-changed=../micro-engine/src/ops.rs");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let bytes = micro_engine::example_lstm_model()
        .to_bytes(micro_engine::SCHEMA_VERSION)
        .expect("Failed to serialize example model");

    fs::write(out_dir.join("example_model.bin"), &bytes).expect("Failed to write example model");
}
