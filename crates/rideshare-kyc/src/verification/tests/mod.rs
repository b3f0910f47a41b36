mod common;
mod review;
mod routing;
