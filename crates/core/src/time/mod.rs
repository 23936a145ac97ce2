pub mod kr_market;
