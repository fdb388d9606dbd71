pub mod booking;
pub mod order;
pub mod seat;
pub mod zone;

pub use booking::Booking;
pub use order::Order;
pub use seat::Seat;
pub use zone::Zone;
