mod calls;
mod code_buffer;
