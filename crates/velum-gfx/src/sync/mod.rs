pub mod external;
pub mod fence;
