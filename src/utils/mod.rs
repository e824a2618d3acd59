pub mod channel_url;
