pub mod flash_namespace;
