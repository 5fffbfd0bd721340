mod commands;
mod enforcement;
mod persistence;
