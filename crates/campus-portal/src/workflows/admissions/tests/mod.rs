mod common;
mod documents;
mod routing;
mod support;
