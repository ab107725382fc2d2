pub mod sse;
#[cfg(test)]
pub mod test_utils;
