mod block_cache;
mod settings;
mod system;
