pub mod google;
pub mod taiga;
