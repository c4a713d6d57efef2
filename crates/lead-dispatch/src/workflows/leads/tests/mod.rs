mod common;
mod dispatch;
mod routing;
