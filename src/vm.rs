//! Stack VM: a single-threaded interpreter over a bytecode program carried
//! in a transaction's `data` field.
//!
//! Grounded on `core/vm.go`, redesigned around a tagged [`Value`] instead
//! of Go's `any` stack, whose dynamic typing is the direct cause of
//! several fatal panics on type mismatch in the reference. The wire
//! format is kept byte-for-byte compatible with the original: the
//! instruction at `data[ip]` is executed, and `PUSH_INT`/`PUSH_BYTE` read
//! their operand from `data[ip-1]` (the byte immediately preceding the
//! opcode in the program). Bytes that don't match one of the nine defined
//! opcodes execute as a no-op — this is what lets an operand byte like
//! `0x03` sit in the instruction stream without being misread as an
//! opcode of its own; it is never independently reached as `data[ip]`'s
//! opcode because the byte *after* it (its real opcode) advances `ip` past
//! it every time.

use thiserror::Error;

use crate::contract_state::ContractState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VMError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("division by zero")]
    DivisionByZero,
    #[error("bad opcode")]
    BadOpcode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Byte(u8),
    Bytes(Vec<u8>),
}

impl Value {
    fn as_int(&self) -> Result<i64, VMError> {
        match self {
            Value::Int(v) => Ok(*v),
            _ => Err(VMError::TypeMismatch),
        }
    }

    fn as_byte(&self) -> Result<u8, VMError> {
        match self {
            Value::Byte(b) => Ok(*b),
            _ => Err(VMError::TypeMismatch),
        }
    }

    fn as_bytes(&self) -> Result<&[u8], VMError> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => Err(VMError::TypeMismatch),
        }
    }
}

#[derive(Debug, Default)]
struct Stack {
    data: Vec<Value>,
}

impl Stack {
    fn push(&mut self, v: Value) {
        self.data.push(v);
    }

    fn pop(&mut self) -> Result<Value, VMError> {
        self.data.pop().ok_or(VMError::StackUnderflow)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    PushInt = 0x0A,
    Add = 0x0B,
    PushByte = 0x0C,
    Pack = 0x0D,
    Sub = 0x0E,
    Store = 0x0F,
    Get = 0x10,
    Mul = 0x11,
    Div = 0x12,
}

impl Opcode {
    fn from_byte(b: u8) -> Option<Opcode> {
        match b {
            0x0A => Some(Opcode::PushInt),
            0x0B => Some(Opcode::Add),
            0x0C => Some(Opcode::PushByte),
            0x0D => Some(Opcode::Pack),
            0x0E => Some(Opcode::Sub),
            0x0F => Some(Opcode::Store),
            0x10 => Some(Opcode::Get),
            0x11 => Some(Opcode::Mul),
            0x12 => Some(Opcode::Div),
            _ => None,
        }
    }
}

pub struct VM<'a> {
    data: &'a [u8],
    ip: usize,
    stack: Stack,
    contract_state: &'a ContractState,
}

fn serialize_i64(v: i64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

impl<'a> VM<'a> {
    pub fn new(data: &'a [u8], contract_state: &'a ContractState) -> Self {
        VM {
            data,
            ip: 0,
            stack: Stack::default(),
            contract_state,
        }
    }

    /// Runs the whole program to completion, or returns the first fatal
    /// error encountered.
    pub fn run(&mut self) -> Result<(), VMError> {
        if self.data.is_empty() {
            return Ok(());
        }
        loop {
            let instr = self.data[self.ip];
            self.exec(instr)?;
            self.ip += 1;
            if self.ip >= self.data.len() {
                break;
            }
        }
        Ok(())
    }

    /// For tests: the final top-of-stack value, if any.
    #[cfg(test)]
    fn top(&self) -> Option<&Value> {
        self.stack.data.last()
    }

    fn exec(&mut self, instr: u8) -> Result<(), VMError> {
        let Some(opcode) = Opcode::from_byte(instr) else {
            // Not one of the nine defined opcodes: a harmless operand byte
            // passing through the instruction stream. See module doc.
            return Ok(());
        };
        match opcode {
            Opcode::PushInt => {
                let operand = self.data[self.ip - 1];
                self.stack.push(Value::Int(operand as i64));
            }
            Opcode::PushByte => {
                let operand = self.data[self.ip - 1];
                self.stack.push(Value::Byte(operand));
            }
            Opcode::Add => {
                let b = self.stack.pop()?.as_int()?;
                let a = self.stack.pop()?.as_int()?;
                self.stack.push(Value::Bytes(serialize_i64(a + b)));
            }
            Opcode::Sub => {
                let b = self.stack.pop()?.as_int()?;
                let a = self.stack.pop()?.as_int()?;
                self.stack.push(Value::Bytes(serialize_i64(a - b)));
            }
            Opcode::Mul => {
                let b = self.stack.pop()?.as_int()?;
                let a = self.stack.pop()?.as_int()?;
                self.stack.push(Value::Bytes(serialize_i64(a * b)));
            }
            Opcode::Div => {
                let b = self.stack.pop()?.as_int()?;
                let a = self.stack.pop()?.as_int()?;
                if b == 0 {
                    return Err(VMError::DivisionByZero);
                }
                self.stack.push(Value::Bytes(serialize_i64(a / b)));
            }
            Opcode::Pack => {
                let n = self.stack.pop()?.as_int()?;
                let n = usize::try_from(n).map_err(|_| VMError::TypeMismatch)?;
                let mut bytes = vec![0u8; n];
                for i in 0..n {
                    let b = self.stack.pop()?.as_byte()?;
                    bytes[n - i - 1] = b;
                }
                self.stack.push(Value::Bytes(bytes));
            }
            Opcode::Store => {
                let key = self.stack.pop()?.as_bytes()?.to_vec();
                let value = self.stack.pop()?.as_bytes()?.to_vec();
                self.contract_state.put(key, value);
            }
            Opcode::Get => {
                let key = self.stack.pop()?.as_bytes()?.to_vec();
                let value = self
                    .contract_state
                    .get(&key)
                    .map_err(|_| VMError::StackUnderflow)?;
                self.stack.push(Value::Bytes(value));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_program(data: &[u8], state: &ContractState) -> Result<Vec<u8>, VMError> {
        let mut vm = VM::new(data, state);
        vm.run()?;
        match vm.top() {
            Some(Value::Bytes(b)) => Ok(b.clone()),
            other => panic!("expected Bytes on top of stack, got {other:?}"),
        }
    }

    #[test]
    fn push_add() {
        let state = ContractState::new();
        // push 3, push 2, add -> 5
        let program = [0x03, 0x0A, 0x02, 0x0A, 0x0B];
        let top = run_program(&program, &state).unwrap();
        assert_eq!(top, 5i64.to_le_bytes().to_vec());
    }

    #[test]
    fn push_sub() {
        let state = ContractState::new();
        let program = [0x03, 0x0A, 0x02, 0x0A, 0x0E];
        let top = run_program(&program, &state).unwrap();
        assert_eq!(top, 1i64.to_le_bytes().to_vec());
    }

    #[test]
    fn div_by_zero_is_fatal() {
        let state = ContractState::new();
        let program = [0x04, 0x0A, 0x00, 0x0A, 0x12];
        let mut vm = VM::new(&program, &state);
        assert_eq!(vm.run(), Err(VMError::DivisionByZero));
    }

    #[test]
    fn store_then_get_round_trips_through_pack() {
        let state = ContractState::new();
        // push 3, push 2, sub -> value 1 (bytes)
        // push 'F','O','O', push 3, pack -> key "FOO"
        // store
        let mut program = vec![0x03, 0x0A, 0x02, 0x0A, 0x0E];
        program.extend_from_slice(&[b'F', 0x0C, b'O', 0x0C, b'O', 0x0C, 0x03, 0x0A, 0x0D]);
        program.push(0x0F); // STORE
        let mut vm = VM::new(&program, &state);
        vm.run().unwrap();
        assert_eq!(state.get(b"FOO").unwrap(), 1i64.to_le_bytes().to_vec());

        // second program: rebuild key "FOO" and GET it
        let mut program2 = vec![b'F', 0x0C, b'O', 0x0C, b'O', 0x0C, 0x03, 0x0A, 0x0D];
        program2.push(0x10); // GET
        let top = run_program(&program2, &state).unwrap();
        assert_eq!(top, 1i64.to_le_bytes().to_vec());
    }

    #[test]
    fn pack_preserves_push_order() {
        let state = ContractState::new();
        // push 'A','B','C' then pack 3 -> bytes should be [A,B,C]
        let program = [b'A', 0x0C, b'B', 0x0C, b'C', 0x0C, 0x03, 0x0A, 0x0D];
        let top = run_program(&program, &state).unwrap();
        assert_eq!(top, vec![b'A', b'B', b'C']);
    }

    #[test]
    fn stack_underflow_on_empty_pop() {
        let state = ContractState::new();
        let program = [0x0B]; // ADD with nothing pushed
        let mut vm = VM::new(&program, &state);
        assert_eq!(vm.run(), Err(VMError::StackUnderflow));
    }
}
