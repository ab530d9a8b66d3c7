pub mod service_day;
