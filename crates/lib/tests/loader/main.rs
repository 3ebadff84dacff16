mod common;
mod devices_tests;
mod instance_tests;
mod layers_tests;
