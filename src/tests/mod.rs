//! Test modules for notecrawl
//!
//! Browser-driven flows run against `fake_page::FakePage`; HTTP flows use mockito.

#[cfg(test)]
pub mod carousel_tests;
#[cfg(test)]
pub mod detector_tests;
#[cfg(test)]
pub mod jobs_tests;
#[cfg(test)]
pub mod openai_tests;
