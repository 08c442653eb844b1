pub mod prediction_market;
