//! Presentation layer for the deck.

pub mod terminal;
