//! Obstacle-awareness assistant fusing a depth grid with an ultrasonic ranger
//! into spoken and audible cues.

pub mod assist;
pub mod cli;
