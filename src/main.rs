//! # Voxel Chunk Pipeline Demo
//!
//! Entry point of the headless demo. It simply calls into the library's `run()`.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release -- [config.json]
//! ```

fn main() {
    voxel_chunk_pipeline::run();
}
