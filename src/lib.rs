pub mod archive;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod extract;
pub mod fs_util;
pub mod grouping;
pub mod http;
pub mod library;
pub mod login;
pub mod manager;
pub mod mylist;
pub mod output;
pub mod points;
pub mod purchases;
pub mod session;
pub mod store;
pub mod tui;
