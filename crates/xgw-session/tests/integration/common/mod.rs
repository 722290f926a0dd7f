pub mod mock_venue;
pub mod sink;
