pub mod build_sequential;
pub mod clip_grad;
