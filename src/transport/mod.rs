pub mod keep_alive_stream;
pub mod keep_alive_timer;
pub mod packet_framer;
