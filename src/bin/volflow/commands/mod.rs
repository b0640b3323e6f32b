pub mod conn;
pub mod grad2vol;
