#![allow(dead_code)]

pub mod backends;
pub mod downloader;
pub mod fetcher;
