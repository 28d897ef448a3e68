extern crate bincode;
extern crate chrono;
extern crate clap;
extern crate csv;
#[macro_use] extern crate derive_more;
extern crate parking_lot;
extern crate rayon;
extern crate reqwest;
#[macro_use] extern crate serde_derive;
extern crate serde;
extern crate serde_json;
#[macro_use] extern crate tracing;

pub mod config;
pub mod delegations;
pub mod export;
pub mod fetch;
pub mod index;
pub mod ingest;
pub mod ip;
pub mod lookup;
pub mod reconcile;
pub mod report;
pub mod store;
