//! Data types, operators and opcode selection
//!
//! Opcode selection only looks at the two operand types and the operator.
//! Integer results are promoted to a fixed 32-bit width; assignment keeps
//! the destination's type and silently truncates.

use crate::compiler::bytecode::Opcode;

/// Identifier data types
///
/// Order matters: every numeric type sorts before `Thread`, and anything at
/// or beyond `Thread` is rejected by arithmetic.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DataType {
    /// Signed 8-bit
    #[default]
    Int8 = 0,
    /// Unsigned 8-bit
    Uint8 = 1,
    /// Signed 16-bit
    Int16 = 2,
    /// Unsigned 16-bit
    Uint16 = 3,
    /// Signed 32-bit
    Int32 = 4,
    /// Unsigned 32-bit
    Uint32 = 5,
    /// 32-bit float
    Float = 6,
    /// Thread handle
    Thread = 7,
    /// No value
    Void = 8,
    /// Invalid type
    Err = 9,
}

impl DataType {
    /// Types accepted by arithmetic
    pub fn is_numeric(self) -> bool {
        self < DataType::Thread
    }

    /// Types accepted as `int main(int)` return and parameter types
    pub fn is_integer(self) -> bool {
        self <= DataType::Uint32
    }

    /// Signed integer types that force a signed result
    pub fn is_signed(self) -> bool {
        matches!(self, DataType::Int8 | DataType::Int16 | DataType::Int32)
    }
}

/// Expression operators, in token order
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Assignment
    Store = 0,
    /// `||`
    LogicalOr = 1,
    /// `&&`
    LogicalAnd = 2,
    /// `^`
    Xor = 3,
    /// `|`
    Or = 4,
    /// `&`
    And = 5,
    /// `!`
    Not = 6,
    /// `==`
    Eq = 7,
    /// `!=`
    Neq = 8,
    /// `<`
    Lt = 9,
    /// `>`
    Gt = 10,
    /// `<=`
    Lte = 11,
    /// `>=`
    Gte = 12,
    /// `+`
    Plus = 13,
    /// `-`
    Minus = 14,
    /// `*`
    Times = 15,
    /// `/`
    Div = 16,
    /// `(`
    LParen = 17,
    /// `)`
    RParen = 18,
    /// `[`
    LBrack = 19,
    /// `]`
    RBrack = 20,
    /// Invalid operator
    Err = 21,
}

impl Operator {
    /// Every operator, for exhaustive table checks
    pub const ALL: [Operator; 22] = [
        Operator::Store,
        Operator::LogicalOr,
        Operator::LogicalAnd,
        Operator::Xor,
        Operator::Or,
        Operator::And,
        Operator::Not,
        Operator::Eq,
        Operator::Neq,
        Operator::Lt,
        Operator::Gt,
        Operator::Lte,
        Operator::Gte,
        Operator::Plus,
        Operator::Minus,
        Operator::Times,
        Operator::Div,
        Operator::LParen,
        Operator::RParen,
        Operator::LBrack,
        Operator::RBrack,
        Operator::Err,
    ];

    /// Operators that combine two operands into an instruction
    pub fn is_binary(self) -> bool {
        (self as u8) <= (Operator::Div as u8)
    }
}

fn store_opcode(left: DataType) -> Opcode {
    match left {
        DataType::Int8 => Opcode::Stri8,
        DataType::Uint8 => Opcode::Stru8,
        DataType::Int16 => Opcode::Stri16,
        DataType::Uint16 => Opcode::Stru16,
        DataType::Int32 => Opcode::Stri32,
        DataType::Uint32 => Opcode::Stru32,
        DataType::Float => Opcode::Strf,
        DataType::Thread | DataType::Void | DataType::Err => Opcode::Err,
    }
}

fn operator_opcode(operator: Operator, float: bool) -> Opcode {
    let pick = |int: Opcode, flt: Opcode| if float { flt } else { int };
    match operator {
        Operator::LogicalOr => Opcode::Lor,
        Operator::LogicalAnd => Opcode::Land,
        Operator::Xor => Opcode::Xor,
        Operator::Or => Opcode::Or,
        Operator::And => Opcode::And,
        Operator::Not => Opcode::Not,
        Operator::Eq => Opcode::Eq,
        Operator::Neq => Opcode::Neq,
        Operator::Lt => Opcode::Lt,
        Operator::Gt => Opcode::Gt,
        Operator::Lte => Opcode::Lte,
        Operator::Gte => Opcode::Gte,
        Operator::Plus => pick(Opcode::Addi, Opcode::Addf),
        Operator::Minus => pick(Opcode::Subi, Opcode::Subf),
        Operator::Times => pick(Opcode::Muli, Opcode::Mulf),
        Operator::Div => pick(Opcode::Divi, Opcode::Divf),
        Operator::Store
        | Operator::LParen
        | Operator::RParen
        | Operator::LBrack
        | Operator::RBrack
        | Operator::Err => Opcode::Err,
    }
}

/// Select the opcode for `left operator right`.
///
/// Returns `Opcode::Err` for illegal combinations. A thread handle may only
/// appear as both sides of an assignment.
pub fn generate_opcode(left: DataType, right: DataType, operator: Operator) -> Opcode {
    if left > DataType::Thread || right > DataType::Thread {
        return Opcode::Err;
    }
    match operator {
        Operator::Store => {
            if left == DataType::Thread || right == DataType::Thread {
                if left == DataType::Thread && right == DataType::Thread {
                    Opcode::Strth
                } else {
                    Opcode::Err
                }
            } else {
                store_opcode(left)
            }
        }
        op if op.is_binary() => {
            if left == DataType::Thread || right == DataType::Thread {
                return Opcode::Err;
            }
            operator_opcode(op, left == DataType::Float || right == DataType::Float)
        }
        _ => Opcode::Err,
    }
}

/// Compute the data type of `left operator right`.
///
/// Assignment keeps the destination type; everything else is float if
/// either side is float, otherwise a 32-bit integer that is signed when
/// either side is signed.
pub fn resulting_data_type(left: DataType, right: DataType, operator: Operator) -> DataType {
    if left == DataType::Thread && right == DataType::Thread && operator == Operator::Store {
        return DataType::Thread;
    }
    if left >= DataType::Thread || right >= DataType::Thread || !operator.is_binary() {
        return DataType::Err;
    }
    if left == DataType::Float || right == DataType::Float {
        return DataType::Float;
    }
    if operator == Operator::Store {
        return left;
    }
    if left.is_signed() || right.is_signed() {
        DataType::Int32
    } else {
        DataType::Uint32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TYPES: [DataType; 10] = [
        DataType::Int8,
        DataType::Uint8,
        DataType::Int16,
        DataType::Uint16,
        DataType::Int32,
        DataType::Uint32,
        DataType::Float,
        DataType::Thread,
        DataType::Void,
        DataType::Err,
    ];

    #[test]
    fn test_reference_examples() {
        assert_eq!(generate_opcode(DataType::Int8, DataType::Float, Operator::Plus), Opcode::Addf);
        assert_eq!(resulting_data_type(DataType::Int8, DataType::Float, Operator::Plus), DataType::Float);

        assert_eq!(generate_opcode(DataType::Uint16, DataType::Uint16, Operator::Plus), Opcode::Addi);
        assert_eq!(resulting_data_type(DataType::Uint16, DataType::Uint16, Operator::Plus), DataType::Uint32);

        assert_eq!(generate_opcode(DataType::Thread, DataType::Thread, Operator::Store), Opcode::Strth);
        assert_eq!(resulting_data_type(DataType::Thread, DataType::Thread, Operator::Store), DataType::Thread);

        assert_eq!(generate_opcode(DataType::Thread, DataType::Int8, Operator::Plus), Opcode::Err);
        assert_eq!(resulting_data_type(DataType::Thread, DataType::Int8, Operator::Plus), DataType::Err);
    }

    #[test]
    fn test_store_uses_left_type() {
        assert_eq!(generate_opcode(DataType::Uint8, DataType::Int32, Operator::Store), Opcode::Stru8);
        assert_eq!(generate_opcode(DataType::Int16, DataType::Float, Operator::Store), Opcode::Stri16);
        assert_eq!(generate_opcode(DataType::Float, DataType::Int8, Operator::Store), Opcode::Strf);
        assert_eq!(resulting_data_type(DataType::Uint8, DataType::Int32, Operator::Store), DataType::Uint8);
        assert_eq!(generate_opcode(DataType::Thread, DataType::Int32, Operator::Store), Opcode::Err);
        assert_eq!(generate_opcode(DataType::Int32, DataType::Thread, Operator::Store), Opcode::Err);
    }

    #[test]
    fn test_signed_promotion() {
        assert_eq!(resulting_data_type(DataType::Int8, DataType::Uint32, Operator::Times), DataType::Int32);
        assert_eq!(resulting_data_type(DataType::Uint8, DataType::Uint32, Operator::Lt), DataType::Uint32);
        assert_eq!(generate_opcode(DataType::Int32, DataType::Int32, Operator::Lte), Opcode::Lte);
        assert_eq!(generate_opcode(DataType::Float, DataType::Float, Operator::Eq), Opcode::Eq);
        assert_eq!(generate_opcode(DataType::Int8, DataType::Int8, Operator::Not), Opcode::Not);
    }

    #[test]
    fn test_matrix_rejects_control_types() {
        for &left in &TYPES {
            for &right in &TYPES {
                for &op in &Operator::ALL {
                    let opcode = generate_opcode(left, right, op);
                    let ty = resulting_data_type(left, right, op);
                    let thread_store =
                        left == DataType::Thread && right == DataType::Thread && op == Operator::Store;
                    if thread_store {
                        assert_eq!((opcode, ty), (Opcode::Strth, DataType::Thread));
                    } else if !left.is_numeric() || !right.is_numeric() || !op.is_binary() {
                        assert_eq!(opcode, Opcode::Err, "{:?} {:?} {:?}", left, op, right);
                        assert_eq!(ty, DataType::Err, "{:?} {:?} {:?}", left, op, right);
                    } else {
                        assert_ne!(opcode, Opcode::Err, "{:?} {:?} {:?}", left, op, right);
                        assert_ne!(ty, DataType::Err, "{:?} {:?} {:?}", left, op, right);
                    }
                }
            }
        }
    }

    #[test]
    fn test_float_variants_only_for_arithmetic() {
        for (op, int, flt) in [
            (Operator::Plus, Opcode::Addi, Opcode::Addf),
            (Operator::Minus, Opcode::Subi, Opcode::Subf),
            (Operator::Times, Opcode::Muli, Opcode::Mulf),
            (Operator::Div, Opcode::Divi, Opcode::Divf),
        ] {
            assert_eq!(generate_opcode(DataType::Int32, DataType::Uint8, op), int);
            assert_eq!(generate_opcode(DataType::Uint8, DataType::Float, op), flt);
        }
        assert_eq!(generate_opcode(DataType::Float, DataType::Int8, Operator::Xor), Opcode::Xor);
    }
}
