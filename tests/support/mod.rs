#![allow(dead_code)]

pub mod bat_table;
