/// Renders a big-endian unsigned integer of any width as a decimal string.
///
/// Leading zero bytes are ignored; an all-zero (or empty) input renders as `"0"`.
pub fn be_bytes_to_decimal(bytes: &[u8]) -> String {
    let mut number: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();

    if number.is_empty() {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(bytes.len() * 3);

    // Schoolbook long division by 10, one byte "digit" at a time.
    while !number.is_empty() {
        let mut remainder: u16 = 0;
        let mut quotient = Vec::with_capacity(number.len());

        for byte in &number {
            let accumulator = (remainder << 8) | u16::from(*byte);
            // PANIC SAFETY: accumulator < 10 * 256, so the quotient fits in a byte.
            #[allow(clippy::cast_possible_truncation)]
            let digit = (accumulator / 10) as u8;
            remainder = accumulator % 10;

            if !(quotient.is_empty() && digit == 0) {
                quotient.push(digit);
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        digits.push(char::from(b'0' + remainder as u8));
        number = quotient;
    }

    digits.iter().rev().collect()
}
