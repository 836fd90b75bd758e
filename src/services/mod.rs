pub mod gemini;
pub mod veo;
