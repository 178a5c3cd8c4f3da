mod backend;

pub use backend::HttpRideAPI;
