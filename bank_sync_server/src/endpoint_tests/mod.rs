mod connections;
mod helpers;
mod reviews;
