// TODO: Support hexadecimal literals so that raw wad constants copied from
// contract sources can be written without converting them by hand.

use ethers::types::U256;
use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, Error, LitFloat, LitInt, Result,
};

/// A non-negative numeric literal in decimal or scientific notation.
struct Number {
    digits: String,
    span: proc_macro2::Span,
}

impl Parse for Number {
    /// This parser uses the LitFloat and LitInt parsers to clean the input.
    fn parse(input: ParseStream) -> Result<Self> {
        if input.peek(LitFloat) {
            let lit = input.parse::<LitFloat>()?;
            Ok(Self {
                digits: lit.base10_digits().to_string(),
                span: lit.span(),
            })
        } else if input.peek(LitInt) {
            let lit = input.parse::<LitInt>()?;
            Ok(Self {
                digits: lit.base10_digits().to_string(),
                span: lit.span(),
            })
        } else {
            Err(input.error("expected a non-negative float or integer literal"))
        }
    }
}

impl Number {
    fn to_u256(&self) -> Result<U256> {
        let overflow = || Error::new(self.span, "literal does not fit in a uint256");

        // Split the cleaned input into a mantissa and an exponent. Any digits
        // after the decimal point count against the exponent.
        let (mantissa, exponent) = match self.digits.split_once('e') {
            Some((mantissa, exponent)) => (mantissa, exponent),
            None => (self.digits.as_str(), "0"),
        };
        let exponent = exponent
            .parse::<u32>()
            .map_err(|_| Error::new(self.span, "exponent must be a non-negative integer"))?;
        let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));

        let mut value = U256::zero();
        for c in whole.chars().chain(fraction.chars()) {
            let d = c
                .to_digit(10)
                .ok_or_else(|| Error::new(self.span, format!("unexpected character: {c}")))?;
            value = value
                .checked_mul(U256::from(10))
                .and_then(|v| v.checked_add(U256::from(d)))
                .ok_or_else(overflow)?;
        }

        // The result must be an integer once the exponent is applied.
        let decimals = fraction.len() as u32;
        if exponent < decimals {
            return Err(Error::new(
                self.span,
                "exponent is too small to produce an integer",
            ));
        }
        let scale = U256::from(10)
            .checked_pow(U256::from(exponent - decimals))
            .ok_or_else(overflow)?;
        value.checked_mul(scale).ok_or_else(overflow)
    }
}

/// Expands a literal such as `1.05e18` into an `ethers::types::U256`.
#[proc_macro]
pub fn uint256(input: TokenStream) -> TokenStream {
    let number = parse_macro_input!(input as Number);
    match number.to_u256() {
        Ok(value) => {
            let bytes: [u8; 32] = value.into();
            quote!(ethers::types::U256::from([ #(#bytes),* ])).into()
        }
        Err(err) => err.to_compile_error().into(),
    }
}

/// Expands a literal such as `0.5e18` into a `FixedPoint`. The caller must
/// have `FixedPoint` in scope.
#[proc_macro]
pub fn fixed(input: TokenStream) -> TokenStream {
    let number = parse_macro_input!(input as Number);
    match number.to_u256() {
        Ok(value) => {
            let bytes: [u8; 32] = value.into();
            quote!(FixedPoint::from([ #(#bytes),* ])).into()
        }
        Err(err) => err.to_compile_error().into(),
    }
}
