mod assertion;

pub use assertion::AccessAssertion;
