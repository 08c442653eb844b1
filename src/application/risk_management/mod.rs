// Position sizing and protective stop maintenance
pub mod sizing_engine;
pub mod trailing_stops;
