pub mod design;
pub mod inspect;
